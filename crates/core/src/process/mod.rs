pub mod executable_resolver;
pub mod process_invoker;
