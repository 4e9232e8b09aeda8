// Storage integration tests

mod synced_test;
