pub(crate) mod args;
pub(crate) mod value_path;
