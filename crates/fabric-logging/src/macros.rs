//! ---
//! fabric_section: "03-logging"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Context-enriched tracing macros."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __fabric_event {
    ($level:expr, $ctx:expr, [$($field:ident = $value:expr),*], $($arg:tt)+) => {{
        let ctx: &$crate::LogContext = $ctx;
        tracing::event!(
            $level,
            $($field = $value,)*
            domain = ctx.domain.unwrap_or(""),
            element = ctx.element.unwrap_or(""),
            router = ctx.router.unwrap_or(""),
            origin = ctx.origin.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational event enriched with a [`LogContext`](crate::LogContext).
#[macro_export]
macro_rules! fabric_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::INFO, &$ctx, [], $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::INFO, &$crate::LogContext::default(), [], $($arg)+)
    };
}

/// Emit a warning enriched with a [`LogContext`](crate::LogContext).
#[macro_export]
macro_rules! fabric_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::WARN, &$ctx, [], $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::WARN, &$crate::LogContext::default(), [], $($arg)+)
    };
}

/// Emit an error enriched with a [`LogContext`](crate::LogContext).
#[macro_export]
macro_rules! fabric_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::ERROR, &$ctx, [], $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__fabric_event!(tracing::Level::ERROR, &$crate::LogContext::default(), [], $($arg)+)
    };
}
