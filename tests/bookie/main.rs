// Bookie integration tests
