//! Dumps the operator's own CRD manifests as YAML, one file per kind
//! (`spec.md` §2). `ClusterServiceVersion` is intentionally absent: this
//! operator creates and reads CSVs but never defines the kind (`spec.md`
//! §1 scope), so there is no `CustomResourceExt` impl to dump for it.

use kube::CustomResourceExt;

use catalog_types::{CatalogSource, InstallPlan, OperatorGroup, Subscription};

fn main() {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "crds".to_string());
    std::fs::create_dir_all(&out_dir).expect("create crds output directory");

    write_crd(&out_dir, "catalogsource.yaml", &CatalogSource::crd());
    write_crd(&out_dir, "subscription.yaml", &Subscription::crd());
    write_crd(&out_dir, "installplan.yaml", &InstallPlan::crd());
    write_crd(&out_dir, "operatorgroup.yaml", &OperatorGroup::crd());
}

fn write_crd(out_dir: &str, file_name: &str, crd: &k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition) {
    let path = format!("{out_dir}/{file_name}");
    let yaml = serde_yaml::to_string(crd).expect("serialize CRD to YAML");
    std::fs::write(&path, yaml).unwrap_or_else(|e| panic!("write {path}: {e}"));
    println!("wrote {path}");
}
