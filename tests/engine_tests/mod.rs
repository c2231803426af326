mod aggregate_test;
mod common;
mod execute_test;
mod initializer_test;
mod key_rotation_test;
mod registry_test;
