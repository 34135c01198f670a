pub mod logger;
pub mod naming;
pub mod retry;
pub mod validator;
