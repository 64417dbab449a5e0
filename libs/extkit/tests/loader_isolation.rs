#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Two extensions loaded side by side behind composite loaders.

use std::sync::Arc;

use extkit::loader::{
    CompositeLoader, LoaderError, LookupPolicy, LookupStrategy, MapResolver, ResourceResolver,
};

fn host() -> Arc<dyn ResourceResolver> {
    Arc::new(MapResolver::new("host").with("shared.util.Logger", "host logger"))
}

fn extension_loader(name: &str, resources: &[(&str, &str)]) -> CompositeLoader {
    let mut scope = MapResolver::new(name);
    for (id, content) in resources {
        scope.insert(*id, *content);
    }
    let policy = LookupPolicy::builder()
        .rule("shared.*", LookupStrategy::EnclosingFirst)
        .unwrap()
        .default_strategy(LookupStrategy::IsolatedOnly)
        .build();
    CompositeLoader::new(name, Some(host()), vec![Arc::new(scope)], policy).unwrap()
}

#[test]
fn shared_resources_come_from_host_private_ones_stay_private() {
    let ftp = extension_loader(
        "ftp",
        &[("shared.util.Logger", "ftp logger"), ("ext.Widget", "ftp widget")],
    );
    let http = extension_loader("http", &[("ext.Client", "http client")]);

    // The host copy wins even though ftp bundles its own.
    assert_eq!(ftp.load("shared.util.Logger").unwrap().origin, "host");
    assert_eq!(http.load("shared.util.Logger").unwrap().origin, "host");

    assert_eq!(&*ftp.load("ext.Widget").unwrap().content, b"ftp widget");
    assert!(matches!(
        http.load("ext.Widget"),
        Err(LoaderError::NotFound { ref loader, .. }) if loader == "http"
    ));
    assert!(ftp.load("ext.Client").is_err());
}
