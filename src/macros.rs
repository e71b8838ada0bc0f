/// Emits a trace-level event describing one record header, if `trace-more`
/// is enabled.
#[cfg(feature = "trace-more")]
macro_rules! trace_record {
    ($dir:literal, $head:expr) => {{
        let head: $crate::protocol::RecordHeader = $head;
        ::tracing::trace!(
            direction = $dir, request_id = head.request_id, rtype = head.rtype,
            content_length = head.content_length, padding_length = head.padding_length,
            "record framed"
        );
    }};
}
/// Emits a trace-level event describing one record header, if `trace-more`
/// is enabled.
#[cfg(not(feature = "trace-more"))]
macro_rules! trace_record {
    ($dir:literal, $head:expr) => {{
        let _: $crate::protocol::RecordHeader = $head;
    }};
}
pub(crate) use trace_record;
