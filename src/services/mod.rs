pub mod export_api;
