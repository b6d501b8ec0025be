//! 基础设施层：持有文件系统资源，只暴露能力

pub mod archive;
pub mod result_store;

pub use archive::{collect_images, is_archive, is_supported_image, unpack, IMAGE_EXTENSIONS};
pub use result_store::{durable_write, durable_write_with, ResultStore, WriteStrategy, STORE_FILE_NAME};
