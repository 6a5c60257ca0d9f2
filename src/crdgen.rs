use kube::CustomResourceExt;

use predict_app_operator::crd::PredictApp;

fn main() {
    let crd = serde_yaml::to_string(&PredictApp::crd()).unwrap();
    println!("{crd}");
}
