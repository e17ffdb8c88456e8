use crate::{
    http_client::{ErrorBody, error_response, handle_service_result},
    services::provisioning::{ProvisioningService, WifiCredentialSubmission},
    system_client::{ServiceControl, WifiScanner},
};
use actix_files::NamedFile;
use actix_web::{
    HttpRequest, HttpResponse, Responder,
    error::InternalError,
    http::StatusCode,
    web::{self, Data},
};
use log::{debug, error};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub state: crate::lifecycle::AgentState,
    pub version: &'static str,
}

pub struct Api<Scanner, Control>
where
    Scanner: WifiScanner,
    Control: ServiceControl,
{
    pub provisioning: Arc<ProvisioningService<Scanner, Control>>,
    pub landing_page: PathBuf,
}

impl<Scanner, Control> Clone for Api<Scanner, Control>
where
    Scanner: WifiScanner,
    Control: ServiceControl,
{
    fn clone(&self) -> Self {
        Self {
            provisioning: self.provisioning.clone(),
            landing_page: self.landing_page.clone(),
        }
    }
}

impl<Scanner, Control> Api<Scanner, Control>
where
    Scanner: WifiScanner + 'static,
    Control: ServiceControl + 'static,
{
    pub fn new(
        provisioning: Arc<ProvisioningService<Scanner, Control>>,
        landing_page: PathBuf,
    ) -> Self {
        Api {
            provisioning,
            landing_page,
        }
    }

    /// Register the provisioning routes. `Data<Self>` must be provided by the app.
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
            let response =
                error_response(StatusCode::BAD_REQUEST, "invalid_submission", &err.to_string());
            InternalError::from_response(err, response).into()
        }))
        .route("/", web::get().to(Self::index))
        .route("/networks", web::get().to(Self::networks))
        .route("/submit", web::post().to(Self::submit))
        .route("/status", web::get().to(Self::status))
        .route("/version", web::get().to(Self::version));
    }

    pub async fn index(req: HttpRequest, api: Data<Self>) -> HttpResponse {
        debug!("index() called");

        match api.landing_page() {
            Some(file) => file.into_response(&req),
            None => HttpResponse::NotFound().json(ErrorBody {
                error: "landing_page_missing".to_string(),
                detail: format!("{:?} cannot be opened", api.landing_page),
            }),
        }
    }

    pub async fn networks(api: Data<Self>) -> impl Responder {
        debug!("networks() called");
        handle_service_result(api.provisioning.networks().await, "networks")
    }

    pub async fn submit(
        req: HttpRequest,
        body: web::Json<WifiCredentialSubmission>,
        api: Data<Self>,
    ) -> HttpResponse {
        debug!("submit() called: {body:?}");

        match api.provisioning.submit(&body).await {
            Ok(()) => match api.landing_page() {
                Some(file) => file.into_response(&req),
                None => HttpResponse::Ok().finish(),
            },
            Err(e) => handle_service_result::<()>(Err(e), "submit"),
        }
    }

    pub async fn status(api: Data<Self>) -> impl Responder {
        debug!("status() called");

        HttpResponse::Ok().json(StatusInfo {
            state: api.provisioning.state(),
            version: env!("CARGO_PKG_VERSION"),
        })
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    fn landing_page(&self) -> Option<NamedFile> {
        NamedFile::open(&self.landing_page)
            .inspect_err(|e| error!("failed to open landing page {:?}: {e}", self.landing_page))
            .ok()
    }
}
