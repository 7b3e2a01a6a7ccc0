//! Test suite for the training infrastructure
//!
//! Covers the loss functions, both training loops, checkpoint round trips
//! and the image-folder-to-samples pipeline end to end.

pub mod integration_tests;
pub mod trainer_tests;


pub use test_utils::{
    assert_tensor_close, create_temp_dir, create_test_device, image_batches, quiet_fit,
    quiet_gan_fit,
};
