pub mod credentials;
pub mod inference;
pub mod session;

pub use credentials::{CredentialProvider, ResolvedCredentials};
pub use inference::{BedrockConnector, StreamConnector, StreamError};
pub use session::{AudioSink, Session, SessionSettings};
