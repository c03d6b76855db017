//! Repository layer for data access

pub mod attempt_logs;
pub mod clients;
pub mod mailings;
pub mod messages;

// Re-export concrete repository implementations with simple names
pub use attempt_logs::DbAttemptLogRepository;
pub use clients::DbClientRepository;
pub use mailings::DbMailingRepository;
pub use messages::DbMessageRepository;

// Re-export repository traits
pub use attempt_logs::AttemptLogRepository;
pub use clients::ClientRepository;
pub use mailings::MailingRepository;
pub use messages::MessageRepository;
