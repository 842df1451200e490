use serde::{Deserialize, Serialize};

/// Events the driver forwards from the attached page. Consumers subscribe
/// through [`crate::Driver::subscribe`]; delivery is independent of any
/// command in flight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PageEvent {
    /// `Runtime.consoleAPICalled` or `Runtime.exceptionThrown`.
    Console { level: String, text: String },
    /// `Network.requestWillBeSent`.
    Request {
        request_id: String,
        url: String,
        method: String,
    },
    /// `Network.responseReceived`.
    Response { request_id: String, status: u16 },
    /// The renderer or browser process died underneath us.
    Crashed { reason: String },
    /// The transport stream ended; the browser is gone.
    Closed,
}
