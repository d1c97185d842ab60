//! Screening pipeline logic that needs no I/O: response classification,
//! report data translation, the report lifecycle engine and the party
//! decision aggregator.

pub mod blocked_services;
pub mod classifier;
pub mod decision;
pub mod lifecycle;
pub mod report_data;

pub use classifier::{classify, Classification, ErrorClass};
pub use decision::{
    build_party_decisions, ApplicantReportSnapshot, ApplicantScreeningData, PartyApplicant,
    PartyScreeningDecision, PartyScreeningInput,
};
pub use lifecycle::{
    ChainHead, GracePeriods, InFlight, LifecycleConfig, NewReportRequest, Promotion,
    ReportLifecycle, ReportPlan, Resolution, Termination,
};
pub use report_data::build_report_data;
