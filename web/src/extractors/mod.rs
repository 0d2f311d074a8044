pub mod client_identity;
