// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(test)]
mod tests {
    use localwise::{ApplyUnit, Context, ContextError, Violation, current_unit};
    use test_executors::async_test;

    #[cfg(target_arch = "wasm32")]
    wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_browser);

    struct YieldOnce(bool);

    impl std::future::Future for YieldOnce {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.0 {
                std::task::Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        }
    }

    #[async_test]
    async fn task_is_its_own_unit() {
        let outside = current_unit();
        let task = ApplyUnit::new(async move {
            let first = current_unit();
            YieldOnce(false).await;
            (first, current_unit())
        });
        let expected = task.unit();
        let (first, after_yield) = task.await;

        assert_eq!(first, expected);
        assert_eq!(after_yield, expected);
        assert_ne!(first, outside);
        // the scope is gone once the task is no longer being polled
        assert_eq!(current_unit(), outside);
    }

    #[cfg(not(feature = "unchecked"))]
    #[async_test]
    async fn tasks_on_one_thread_are_isolated() {
        let parent = Context::local();
        parent.with_local_value("k", "thread");

        let shared = parent.clone();
        let local = ApplyUnit::new(async move {
            let local = shared.localize();
            local.with_local_value("k", "task");
            local
        })
        .await;

        assert_eq!(parent.value_as::<&str>("k").as_deref(), Some(&"thread"));
        // the task's overlay belongs to the task, even on the same thread
        let payload = std::panic::catch_unwind(|| local.value("k")).unwrap_err();
        assert!(matches!(
            payload.downcast_ref::<Violation>(),
            Some(Violation::ThreadAffinity { .. })
        ));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[async_test]
    async fn done_resolves_after_cancel() {
        let (ctx, cancel) = Context::background().with_cancel();
        let child = ctx.with_value("k", 1u8).localize();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            cancel.cancel();
        });
        assert_eq!(child.done().await, ContextError::Canceled);
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[async_test]
    async fn done_resolves_at_deadline() {
        let (ctx, _cancel) =
            Context::background().with_timeout(std::time::Duration::from_millis(30));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }
}
