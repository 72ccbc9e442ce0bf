use std::{future::Future, sync::Arc};

/// `Service` trait
pub trait Service {
    type Request;
    type Response;
    type Exception;
    type Future: Future<Output = Result<Self::Response, Self::Exception>> + Send;

    fn call(&self, req: Self::Request) -> Self::Future;
}

// Arc<T>的Service实现，允许在Arc中使用Service
impl<T> Service for Arc<T>
where
    T: Service,
{
    type Request = T::Request;
    type Response = T::Response;
    type Exception = T::Exception;
    type Future = T::Future;

    fn call(&self, req: Self::Request) -> Self::Future {
        (**self).call(req)
    }
}
