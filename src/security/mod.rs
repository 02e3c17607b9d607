pub mod clock;
pub mod github_app;
pub mod token_cache;
pub mod token_refresh;
pub mod vault_client;

pub use clock::{Clock, ManualClock, SystemClock};
pub use github_app::{AccessToken, IssueError, TokenIssuer};
pub use token_cache::{Connectivity, CredentialCache, IntegrationStatus};
pub use vault_client::{Credential, SecretStoreError, VaultClient};
