pub mod callback;
pub mod gateway;
pub mod initiation;
pub mod memory;
pub mod metrics;
pub mod reconciler;
pub mod repository;
pub mod store;
pub mod transaction_id;

pub use callback::CallbackPayload;
pub use gateway::EsewaGateway;
pub use initiation::InitiationService;
pub use memory::InMemoryTransactionStore;
pub use metrics::{get_metrics, init_metrics};
pub use reconciler::{CallbackOutcome, CallbackReconciler, Resolution};
pub use repository::MongoTransactionStore;
pub use store::{StoreError, TransactionStore};
