pub mod insights;
pub mod reconciliation;
pub mod session;

pub use insights::{BillExtraction, DocumentAnalyzer, GeminiAnalyzer, InsightsError};
pub use reconciliation::{
    MutationOutcome, NewRegistration, NewUtility, ReconciliationEngine, RegisterOutcome,
    RemoteWriteTransport, SyncStatus,
};
pub use session::SessionManager;
