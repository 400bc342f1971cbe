pub mod batch;
pub mod blob_store;
pub mod ingress;
pub mod ledger;
pub mod locations;
pub mod media_api;
pub mod processor;
pub mod queue;
pub mod retry;

#[cfg(test)]
pub mod test_support;
