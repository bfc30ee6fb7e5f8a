/// HTTP middleware for vellum-media
use crate::error::AppError;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

/// Bearer-token authentication against the configured API key.
///
/// Every API route runs behind this except the health endpoint and the
/// resumable-upload hooks, which are covered by the session preconditions.
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: Rc<String>,
}

impl ApiKeyAuth {
    pub fn new(key: String) -> Self {
        Self { key: Rc::new(key) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthService {
            service: Rc::new(service),
            key: self.key.clone(),
        }))
    }
}

pub struct ApiKeyAuthService<S> {
    service: Rc<S>,
    key: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let key = self.key.clone();

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "));

            match token {
                // An unconfigured key fails every request rather than
                // leaving the API open.
                Some(token) if !key.is_empty() && token == key.as_str() => {
                    service.call(req).await
                }
                Some(_) => {
                    Err(AppError::Unauthorized("Invalid bearer token".to_string()).into())
                }
                None => Err(AppError::Unauthorized(
                    "Missing Authorization header".to_string(),
                )
                .into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    async fn protected() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn test_rejects_missing_and_wrong_token() {
        let app = test::init_service(
            App::new()
                .wrap(ApiKeyAuth::new("sekrit".to_string()))
                .route("/x", web::get().to(protected)),
        )
        .await;

        let req = test::TestRequest::get().uri("/x").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = test::TestRequest::get()
            .uri("/x")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_accepts_configured_token() {
        let app = test::init_service(
            App::new()
                .wrap(ApiKeyAuth::new("sekrit".to_string()))
                .route("/x", web::get().to(protected)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/x")
            .insert_header(("Authorization", "Bearer sekrit"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn test_empty_key_fails_closed() {
        let app = test::init_service(
            App::new()
                .wrap(ApiKeyAuth::new(String::new()))
                .route("/x", web::get().to(protected)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/x")
            .insert_header(("Authorization", "Bearer "))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
