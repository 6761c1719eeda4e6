pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_config, connect_with_settings, ping, DbPool};
pub use repositories::{
    ConsumedTemp, DocumentRepository, InMemoryApprovalStore, RepositoryError, SqlDocumentRepository,
    SqlTempDocumentRepository, TempDocumentRepository,
};
