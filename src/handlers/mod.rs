// handlers/mod.rs - HTTP handlers
//
// public:    service description and health, no token involved
// session:   route resolution for the caller's bearer token (absent token = signed out)
// functions: role self-assignment, bearer token required

pub mod functions;
pub mod public;
pub mod session;
