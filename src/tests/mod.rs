
mod test_local_bucket_store;
