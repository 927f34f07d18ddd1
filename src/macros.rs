macro_rules! meta {
    ($($lhs:ident : $rhs:expr),*) => {{
        ::kube::core::ObjectMeta {
            $($lhs : $rhs),*,

            ..Default::default()
        }
    }};
}

/// The fixed selector shared by every plex deployment and its pods
macro_rules! labels {
    () => {{
        ::std::collections::BTreeMap::<String, String>::from_iter([
            ("app".into(), "plex".into()),
            ("tier".into(), "frontend".into()),
            ("environment".into(), "prod".into()),
        ])
    }};
}
