pub mod atomic_file;
pub mod bundle;
pub mod metadata;
pub mod screenshot;
pub mod system_info;
pub mod upload_store;
