use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Fixed set of system metadata fields collected for every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    EngineVersion,
    ReporterVersion,
    OperatingSystem,
    OsFamily,
    Architecture,
    CpuModel,
    CpuCores,
    GpuModel,
    TotalMemoryBytes,
    CapturedAt,
    SessionDurationSecs,
}

impl MetadataField {
    pub const ALL: [MetadataField; 11] = [
        MetadataField::EngineVersion,
        MetadataField::ReporterVersion,
        MetadataField::OperatingSystem,
        MetadataField::OsFamily,
        MetadataField::Architecture,
        MetadataField::CpuModel,
        MetadataField::CpuCores,
        MetadataField::GpuModel,
        MetadataField::TotalMemoryBytes,
        MetadataField::CapturedAt,
        MetadataField::SessionDurationSecs,
    ];
}

/// Value of one metadata field.
///
/// `Unavailable` is explicit so consumers can tell "not collected" apart
/// from an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Available(String),
    Unavailable,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable => None,
        }
    }
}

/// System/hardware metadata attached to a report.
///
/// Always carries every `MetadataField`; fields that could not be collected
/// hold `FieldValue::Unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<MetadataField, FieldValue>", into = "BTreeMap<MetadataField, FieldValue>")]
pub struct SystemMetadata {
    fields: BTreeMap<MetadataField, FieldValue>,
}

impl SystemMetadata {
    /// Creates metadata with every field marked unavailable.
    pub fn new() -> Self {
        Self {
            fields: MetadataField::ALL
                .iter()
                .map(|f| (*f, FieldValue::Unavailable))
                .collect(),
        }
    }

    pub fn set(&mut self, field: MetadataField, value: impl Into<String>) {
        self.fields.insert(field, FieldValue::Available(value.into()));
    }

    /// Sets the field when `value` is `Some`, marks it unavailable otherwise.
    pub fn set_optional(&mut self, field: MetadataField, value: Option<String>) {
        let value = value.map(FieldValue::Available).unwrap_or(FieldValue::Unavailable);
        self.fields.insert(field, value);
    }

    pub fn mark_unavailable(&mut self, field: MetadataField) {
        self.fields.insert(field, FieldValue::Unavailable);
    }

    pub fn get(&self, field: MetadataField) -> &FieldValue {
        self.fields.get(&field).unwrap_or(&FieldValue::Unavailable)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetadataField, &FieldValue)> {
        self.fields.iter()
    }
}

impl Default for SystemMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BTreeMap<MetadataField, FieldValue>> for SystemMetadata {
    fn from(parsed: BTreeMap<MetadataField, FieldValue>) -> Self {
        let mut metadata = Self::new();
        metadata.fields.extend(parsed);
        metadata
    }
}

impl From<SystemMetadata> for BTreeMap<MetadataField, FieldValue> {
    fn from(metadata: SystemMetadata) -> Self {
        metadata.fields
    }
}

/// One attached file of the bundle's metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub file_name: String,
    pub byte_size: u64,
    pub sha256: String,
    pub content_type: String,
    /// Clip only: the encoder was killed or failed, so it may be truncated.
    #[serde(default)]
    pub best_effort: bool,
}

/// Release a report is filed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReleaseTarget {
    /// An existing release on the server.
    Id(String),
    /// A release label such as "v1.2.3"; the server creates it if unknown.
    Label(String),
}

impl ReleaseTarget {
    /// An id takes precedence over a label. Blank values count as unset.
    pub fn resolve(id: Option<&str>, label: Option<&str>) -> Option<Self> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned);
        present(id)
            .map(Self::Id)
            .or_else(|| present(label).map(Self::Label))
    }
}

/// The metadata document stored in (and uploaded with) every bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub report_id: String,
    pub created_at: String,
    pub description: String,
    pub steps_to_reproduce: Option<String>,
    pub metadata: SystemMetadata,
    pub clip: Option<AttachmentDescriptor>,
    pub screenshot: Option<AttachmentDescriptor>,
    pub log_file: Option<String>,
    pub log_line_count: usize,
    #[serde(default)]
    pub release: Option<ReleaseTarget>,
}

/// A finalized, immutable bug report package on local storage.
///
/// Cheap to clone; all clones share the same snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBundle {
    inner: Arc<BundleContents>,
}

#[derive(Debug, PartialEq)]
struct BundleContents {
    directory: PathBuf,
    document: ReportDocument,
    logs: Vec<String>,
}

impl ReportBundle {
    pub(crate) fn from_parts(directory: PathBuf, document: ReportDocument, logs: Vec<String>) -> Self {
        Self {
            inner: Arc::new(BundleContents {
                directory,
                document,
                logs,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.document.report_id
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn clip_path(&self) -> Option<PathBuf> {
        self.attachment_path(self.inner.document.clip.as_ref())
    }

    pub fn screenshot_path(&self) -> Option<PathBuf> {
        self.attachment_path(self.inner.document.screenshot.as_ref())
    }

    /// The file transferred in chunks: the clip, else the screenshot.
    /// Reports with neither upload only their metadata document.
    pub fn payload(&self) -> Option<&AttachmentDescriptor> {
        let document = &self.inner.document;
        document.clip.as_ref().or(document.screenshot.as_ref())
    }

    pub fn payload_path(&self) -> Option<PathBuf> {
        self.attachment_path(self.payload())
    }

    /// Total bytes an upload of this bundle transfers.
    pub fn payload_size(&self) -> u64 {
        self.payload().map_or(0, |p| p.byte_size)
    }

    pub fn document(&self) -> &ReportDocument {
        &self.inner.document
    }

    pub fn logs(&self) -> &[String] {
        &self.inner.logs
    }

    pub fn description(&self) -> &str {
        &self.inner.document.description
    }

    pub fn metadata(&self) -> &SystemMetadata {
        &self.inner.document.metadata
    }

    fn attachment_path(&self, attachment: Option<&AttachmentDescriptor>) -> Option<PathBuf> {
        attachment.map(|a| self.inner.directory.join(&a.file_name))
    }
}

/// What the UI receives once a report has been accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub report_id: String,
    pub confirmation_id: String,
    pub clip_best_effort: bool,
}
