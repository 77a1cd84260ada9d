use tracing::warn;
use windows::Win32::Graphics::Dxgi::*;

/// Logs and clears everything the debug layer queued up.
pub fn print_debug_messages(info_queue: Option<&IDXGIInfoQueue>) {
    let Some(queue) = info_queue else {
        warn!("DXGI info queue not available");
        return;
    };

    let num_messages = unsafe { queue.GetNumStoredMessages(DXGI_DEBUG_ALL) };
    warn!(num_messages, "DXGI debug messages");

    for i in 0..num_messages {
        let mut message_size: usize = 0;
        if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, None, &mut message_size) }.is_err() {
            warn!("Error getting size for message {i}");
            continue;
        }

        // u64 storage keeps the message header aligned.
        let mut message_buffer = vec![0u64; message_size.div_ceil(8)];
        let p_message = message_buffer.as_mut_ptr() as *mut DXGI_INFO_QUEUE_MESSAGE;

        if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, Some(p_message), &mut message_size) }
            .is_err()
        {
            warn!("Error getting message data for message {i}");
            continue;
        }

        let message = unsafe { &*p_message };
        let description = unsafe {
            std::slice::from_raw_parts(
                message.pDescription as *const u8,
                message.DescriptionByteLength,
            )
        };
        let description = String::from_utf8_lossy(description)
            .trim_end_matches('\0')
            .trim()
            .to_owned();

        let severity = match message.Severity {
            DXGI_INFO_QUEUE_MESSAGE_SEVERITY_CORRUPTION => "CORRUPTION",
            DXGI_INFO_QUEUE_MESSAGE_SEVERITY_ERROR => "ERROR",
            DXGI_INFO_QUEUE_MESSAGE_SEVERITY_WARNING => "WARNING",
            DXGI_INFO_QUEUE_MESSAGE_SEVERITY_INFO => "INFO",
            DXGI_INFO_QUEUE_MESSAGE_SEVERITY_MESSAGE => "MESSAGE",
            _ => "UNKNOWN",
        };

        warn!("DXGI Debug [{} ID:{}]: {}", severity, message.ID, description);
    }

    unsafe { queue.ClearStoredMessages(DXGI_DEBUG_ALL) };
}
