use std::any::type_name;

/// The bare Kubernetes kind name for a Rust type, e.g. `k8s_openapi::api::core::v1::Pod`
/// becomes `"Pod"`. Used for log lines and the `/debug` surface where the fully
/// qualified Rust path would be noise.
#[inline]
pub fn short_type_name<K>() -> Option<&'static str> {
    type_name::<K>().split("::").last()
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;

    #[test]
    fn strips_the_module_path() {
        assert_eq!(short_type_name::<Pod>(), Some("Pod"));
    }
}
