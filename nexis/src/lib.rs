pub mod cache_common;
pub mod clahe;
pub mod color_space;
pub mod color_utils;
pub mod config;
pub mod detection;
pub mod detection_obj;
pub mod enhancement;
pub mod image_input;
pub mod model_access;
pub mod model_processing;
pub mod onnx_session;
pub mod output_manager;
pub mod path_validation;
pub mod progress;
pub mod run_report;
pub mod super_resolution;
pub mod upscale;
pub mod viewer;
pub mod yolo_postprocessing;
pub mod yolo_preprocessing;
