pub(crate) mod context;

mod test_append;
mod test_iterator;
