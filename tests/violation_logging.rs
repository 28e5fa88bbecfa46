// SPDX-License-Identifier: MIT OR Apache-2.0

logwise::declare_logging_domain!();

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use localwise::{Context, Violation};
    use logwise::InMemoryLogger;
    use logwise::global_logger::{global_loggers, set_global_loggers};

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::*;

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn violations_are_logged_before_panicking() {
        let logger = Arc::new(InMemoryLogger::new());
        let original = global_loggers();
        set_global_loggers(vec![logger.clone()]);

        let ctx = Context::background();
        let payload = std::panic::catch_unwind(|| ctx.with_local_value("k", 1)).unwrap_err();

        set_global_loggers(original);

        assert_eq!(
            payload.downcast_ref::<Violation>(),
            Some(&Violation::NotLocalized)
        );
        let logs = logger.drain_logs();
        assert!(logs.contains("localwise violation"), "{logs}");
        assert!(logs.contains("not localized"), "{logs}");
    }
}
