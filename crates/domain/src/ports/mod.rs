use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

pub mod identity;
pub mod object_store;
pub mod record_store;
