mod api_test;
mod service_manager_test;
mod support;
