pub mod config;
pub mod domain;
pub mod errors;
pub mod screening;
pub mod vendor;

pub use chrono;

pub use domain::applicant::{
    ApplicantId, ApplicationData, LeaseType, MemberType, PartyId, PropertyId, TenantId,
};
pub use domain::report::{
    ApplicantReport, ApplicantReportId, BlockedReason, ReportData, ReportKind, ReportStatus,
};
pub use domain::tracking::{
    ReportRequest, ReportRequestId, ReportResponse, ReportResponseId, RequestType,
    ScreeningResponseStatus, ServiceState, ServiceStatusMap,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use vendor::VendorResponse;
