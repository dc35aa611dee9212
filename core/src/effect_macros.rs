//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when reducers build timers and async work.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust
/// use rolling_qr_core::async_effect;
///
/// #[derive(Debug)]
/// enum Action {
///     Loaded(u32),
/// }
///
/// let effect = async_effect! {
///     Some(Action::Loaded(7))
/// };
/// assert!(matches!(effect, rolling_qr_core::effect::Effect::Future(_)));
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use rolling_qr_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(1),
///     action: GeneratorAction::Tick { generation }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create a cancellable `Effect::Delay` registered under an id
///
/// # Example
///
/// ```rust,ignore
/// use rolling_qr_core::cancellable_delay;
///
/// cancellable_delay! {
///     id: EXPIRY_TIMER,
///     duration: Duration::from_secs(600),
///     action: GeneratorAction::SessionExpired { generation }
/// }
/// ```
#[macro_export]
macro_rules! cancellable_delay {
    (
        id: $id:expr,
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Cancellable {
            id: $id,
            effect: ::std::boxed::Box::new($crate::delay! {
                duration: $duration,
                action: $action
            }),
        }
    };
}
