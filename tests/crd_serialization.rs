use kube::CustomResourceExt;
use predict_app_operator::crd::{
    AppPhase, PredictApp, PredictAppSpec, PredictAppStatus, ServiceType,
};
use serde_json::json;

#[test]
fn spec_uses_camel_case_wire_names() {
    let spec = PredictAppSpec {
        app_image: "app:v1".into(),
        container_port: 8080,
        replicas: Some(2),
        resources: None,
        service_port: 8001,
        service_type: Some(ServiceType::NodePort),
    };
    let j = serde_json::to_value(&spec).unwrap();
    assert_eq!(
        j,
        json!({
            "appImage": "app:v1",
            "containerPort": 8080,
            "replicas": 2,
            "servicePort": 8001,
            "serviceType": "NodePort"
        })
    );
    let back: PredictAppSpec = serde_json::from_value(j).unwrap();
    assert_eq!(back, spec);
}

#[test]
fn optional_fields_may_be_omitted() {
    let spec: PredictAppSpec =
        serde_json::from_value(json!({"appImage": "app:v1", "containerPort": 8080})).unwrap();
    assert_eq!(spec.replicas, None);
    assert_eq!(spec.service_port, 0);
    assert_eq!(spec.service_type, None);
    assert!(spec.resources_empty());
}

#[test]
fn service_type_tolerates_empty_and_unknown_names() {
    let spec: PredictAppSpec = serde_json::from_value(json!({
        "appImage": "app:v1",
        "containerPort": 8080,
        "serviceType": ""
    }))
    .unwrap();
    assert_eq!(spec.service_type, None);

    let spec: PredictAppSpec = serde_json::from_value(json!({
        "appImage": "app:v1",
        "containerPort": 8080,
        "serviceType": "Ingress"
    }))
    .unwrap();
    assert_eq!(spec.service_type, Some(ServiceType::Other("Ingress".into())));
    assert_eq!(serde_json::to_value(&spec).unwrap()["serviceType"], "Ingress");
}

#[test]
fn crd_schema_takes_service_type_as_plain_string() {
    let crd = serde_json::to_value(PredictApp::crd()).unwrap();
    let spec = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"];
    let field = &spec["properties"]["serviceType"];
    assert_eq!(field["type"], "string");
    assert!(field.get("enum").is_none());
}

#[test]
fn status_serializes_phase_and_endpoint() {
    let status = PredictAppStatus {
        ready_replicas: 1,
        service_endpoint: Some("lstm.ml.svc.cluster.local:8001".into()),
        phase: Some(AppPhase::Running),
        last_update_time: None,
    };
    assert_eq!(
        serde_json::to_value(&status).unwrap(),
        json!({
            "readyReplicas": 1,
            "serviceEndpoint": "lstm.ml.svc.cluster.local:8001",
            "phase": "Running"
        })
    );
}

#[test]
fn crd_is_namespaced_with_status_subresource() {
    let crd = PredictApp::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("predictapps.apps.predictor.dev"));
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["pa".to_string()]));
    let version = &crd.spec.versions[0];
    assert!(version.subresources.as_ref().unwrap().status.is_some());
}
