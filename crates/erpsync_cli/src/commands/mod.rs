pub(crate) mod check;
pub(crate) mod meta;
pub(crate) mod run;
pub(crate) mod shared;
