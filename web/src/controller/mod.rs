pub(crate) mod clerk_webhook_controller;
pub(crate) mod health_check_controller;
