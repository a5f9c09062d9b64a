use crate::domain::table::{PartitionEntry, TableDefinition};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Key/value blob storage addressed by `/` separated relative keys.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn delete_file(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;
    fn rename_file(
        &self,
        from: &str,
        to: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn list_files(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// 試算表類的資料來源：回傳整張工作表的儲存格字串
#[async_trait]
pub trait TabularProvider: Send + Sync {
    fn describe(&self) -> String;

    /// Row-major cell text. Trailing empty cells may be omitted per row.
    async fn read_grid(&self) -> Result<Vec<Vec<String>>>;
}

/// Table metastore. A partition is queryable once the table definition listing it is
/// published.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<TableDefinition>>;

    /// Replaces the stored definition (columns and partition list) in one change.
    /// `recreate` marks a definition that supersedes the old table instead of altering it.
    async fn publish_table(&self, definition: &TableDefinition, recreate: bool) -> Result<()>;

    async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<PartitionEntry>>;
}
