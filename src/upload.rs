//! Upload contract (spec §6). The ingest pipeline produces provenance
//! JSON and slice PNGs; handing them off to a remote archive is modeled
//! as a trait so the orchestrator can be driven in tests without a live
//! server, matching the separation between `history.py`/`make_slices.py`
//! (which only ever produce bytes) and `simple_upload.py`/
//! `update_plexus.py` (which transport them) in the Python prototype. No
//! transport is implemented here — this crate's Non-goals exclude the
//! network client itself.

use crate::error::Result;

/// One piece of output content destined for upload: a file name and its
/// bytes.
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

/// Accepts a dataset's provenance record and its slice attachments. A
/// real implementation would authenticate with and post to an archive
/// service; this crate only defines the seam.
pub trait UploadClient {
    fn post_update(&mut self, sample: &str, attachments: &[Attachment]) -> Result<()>;
}

/// An `UploadClient` that records what it was asked to upload instead of
/// sending it anywhere, useful for dry runs and tests.
#[derive(Default)]
pub struct RecordingClient {
    pub calls: Vec<(String, Vec<String>)>,
}

impl UploadClient for RecordingClient {
    fn post_update(&mut self, sample: &str, attachments: &[Attachment]) -> Result<()> {
        let names = attachments.iter().map(|a| a.name.clone()).collect();
        self.calls.push((sample.to_string(), names));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_client_captures_attachment_names() {
        let mut client = RecordingClient::default();
        client
            .post_update(
                "sample-1",
                &[Attachment {
                    name: "sliceZ32_sample.png".into(),
                    content: vec![1, 2, 3],
                }],
            )
            .unwrap();
        assert_eq!(client.calls.len(), 1);
        assert_eq!(client.calls[0].0, "sample-1");
        assert_eq!(client.calls[0].1, vec!["sliceZ32_sample.png".to_string()]);
    }
}
