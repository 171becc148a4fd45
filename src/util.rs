pub(crate) use task::*;

mod task;
