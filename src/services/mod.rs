pub mod api_service;
pub mod auth_service;
pub mod config_service;
pub mod file_service;
pub mod generation_service;
pub mod sse_service;
