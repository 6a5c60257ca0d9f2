//! Admission webhook for `PredictApp`.
//!
//! The API server calls the mutating endpoint first, then the validating one,
//! both synchronously before the record is persisted. A rejected record is
//! never stored, so the reconciler only ever sees defaulted, valid specs.

mod defaulter;
mod validator;

pub use defaulter::Defaulter;
pub use validator::{ValidationError, Validator};

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};

use crate::crd::PredictApp;

pub const MUTATE_PATH: &str = "/mutate-predictapp";
pub const VALIDATE_PATH: &str = "/validate-predictapp";

#[derive(Clone, Debug, Default)]
pub struct WebhookState {
    pub defaulter: Defaulter,
    pub validator: Validator,
}

pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_handler))
        .route(VALIDATE_PATH, post(validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook router, over TLS when a certificate pair is given.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    tls: Option<(PathBuf, PathBuf)>,
) -> std::io::Result<()> {
    match tls {
        Some((cert, key)) => {
            let config = RustlsConfig::from_pem_file(cert, key).await?;
            info!(%addr, "starting admission webhook server (https)");
            axum_server::bind_rustls(addr, config)
                .serve(router.into_make_service())
                .await
        }
        None => {
            warn!(%addr, "starting admission webhook server without TLS");
            axum_server::bind(addr)
                .serve(router.into_make_service())
                .await
        }
    }
}

async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate(&state.defaulter, &req).into_review())
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&state.validator, &req).into_review())
}

fn parse_app(req: &AdmissionRequest<DynamicObject>) -> Result<Option<PredictApp>, String> {
    match &req.object {
        None => Ok(None),
        Some(obj) => obj
            .clone()
            .try_parse::<PredictApp>()
            .map(Some)
            .map_err(|e| format!("expected a PredictApp object: {e}")),
    }
}

/// Apply the defaulter and answer with the resulting JSON patch.
pub fn mutate(defaulter: &Defaulter, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    let mut app = match parse_app(req) {
        Ok(Some(app)) => app,
        Ok(None) => return response,
        Err(msg) => {
            warn!(uid = %req.uid, %msg, "rejecting malformed object");
            return response.deny(msg);
        }
    };
    info!(name = %req.name, namespace = ?req.namespace, "defaulting PredictApp");

    let before = match serde_json::to_value(&app) {
        Ok(v) => v,
        Err(e) => return response.deny(format!("serialization error: {e}")),
    };
    defaulter.apply(&mut app.spec);
    let after = match serde_json::to_value(&app) {
        Ok(v) => v,
        Err(e) => return response.deny(format!("serialization error: {e}")),
    };

    let patch = json_patch::diff(&before, &after);
    if patch.0.is_empty() {
        return response;
    }
    match response.clone().with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "failed to serialize patch");
            response.deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Admit or deny the record. Deletes are always admitted.
pub fn validate(validator: &Validator, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    if matches!(req.operation, Operation::Delete | Operation::Connect) {
        return response;
    }

    let app = match parse_app(req) {
        Ok(Some(app)) => app,
        Ok(None) => return response.deny("request carries no object"),
        Err(msg) => {
            warn!(uid = %req.uid, %msg, "rejecting malformed object");
            return response.deny(msg);
        }
    };
    info!(name = %req.name, operation = ?req.operation, "validating PredictApp");

    match validator.validate(&app.spec) {
        Ok(()) => response,
        Err(e) => {
            info!(name = %req.name, reason = %e, "PredictApp rejected");
            let mut denied = response.deny(e.to_string());
            denied.warnings = Some(vec![
                "PredictApp admission webhook rejected the spec".to_string(),
            ]);
            denied
        }
    }
}
