use crate::models::error::TransportError;
use crate::models::report::ReportBundle;

/// Wire protocol to the remote collection endpoint.
///
/// An upload is opened once (sending the metadata document), filled with
/// byte-range chunks in offset order, then confirmed.
pub trait UploadTransport: Send + Sync {
    /// URL recorded as the task destination.
    fn destination(&self) -> String;

    /// Registers the report and returns the server's upload id.
    fn open(&self, bundle: &ReportBundle) -> Result<String, TransportError>;

    /// Sends `data` at `offset` and returns the end offset the server now
    /// holds.
    fn send_chunk(
        &self,
        upload_id: &str,
        offset: u64,
        total: u64,
        data: &[u8],
    ) -> Result<u64, TransportError>;

    /// Finalizes the upload and returns the report confirmation id.
    fn confirm(&self, upload_id: &str) -> Result<String, TransportError>;
}
