pub mod signature;

pub use signature::{
    SignatureError, canonical_message, sign_fields, signed_field_names, verify_fields,
};
