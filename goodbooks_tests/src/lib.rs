//! Black box tests run against a deployed server with loaded data,
//! e.g. `GOODBOOKS_URL=http://127.0.0.1:8080 cargo test --features system_tests`
