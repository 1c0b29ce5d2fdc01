//! Authentication: JWT issuance/verification, password hashing, and the
//! `CurrentUser` request extractor.

mod extractor;
mod jwt;
mod password;

pub use extractor::CurrentUser;
pub use jwt::{Claims, issue_token, verify_token};
pub use password::{hash_password, verify_password};
