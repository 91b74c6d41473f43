/// Step-by-step fault tracing, compiled in with the `trace` feature.
macro_rules! trace {
    ($($arg:tt)*) => {{
        if cfg!(feature = "trace") {
            pagesrv_shared::println!($($arg)*);
        }
    }};
}
