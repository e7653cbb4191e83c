//! REST clients for the Firebase Auth (identitytoolkit) and Cloud Firestore
//! document APIs. Transport only — the chat semantics live in the consumer.

mod auth;
mod firestore;

pub use auth::{AuthApiError, AuthClient, SessionInfo};
pub use firestore::{FirestoreClient, FirestoreError, FsDocument, FsValue};
