//! Screening workflows on top of the report store: submitting reports,
//! handling vendor responses, reconciliation scans and party decisions.

pub mod errors;
pub mod handler;
pub mod outbound;
pub mod party;
pub mod reconciliation;
pub mod requester;

pub use errors::ScreeningError;
pub use handler::{HandlingOutcome, ResponseHandler, VendorDelivery};
pub use outbound::{
    ApplicantReportRequest, LoggingNotifier, LoggingPublisher, PublishError, RecordingNotifier,
    RecordingPublisher, ReportRequestPublisher, ReportStatusNotifier,
};
pub use party::PartyScreeningService;
pub use reconciliation::{ReconciliationReport, ReconciliationScanner, RequestFinding, ScanSettings};
pub use requester::{ApplicantDataChange, ReportRequester, RequestOutcome, SubmissionDraft};
