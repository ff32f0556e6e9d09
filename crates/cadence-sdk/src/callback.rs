use tokio::sync::mpsc;

/// Result of an async step, delivered under its correlation token.
#[derive(Debug, Clone)]
pub struct AsyncCallback {
  pub callback_id: String,
  pub response: serde_json::Value,
}

pub type CallbackReceiver = mpsc::UnboundedReceiver<AsyncCallback>;

/// Handle for delivering async step results to the engine.
///
/// Cloned into steps and external integrations (webhooks, delegate
/// responses); the engine owns the receiving end.
#[derive(Debug, Clone)]
pub struct CallbackSender {
  sender: mpsc::UnboundedSender<AsyncCallback>,
}

impl CallbackSender {
  /// Deliver a response. Returns `false` if the engine loop is gone.
  pub fn send(&self, callback_id: impl Into<String>, response: serde_json::Value) -> bool {
    self
      .sender
      .send(AsyncCallback {
        callback_id: callback_id.into(),
        response,
      })
      .is_ok()
  }
}

/// Create a connected callback sender/receiver pair.
pub fn callback_channel() -> (CallbackSender, CallbackReceiver) {
  let (sender, receiver) = mpsc::unbounded_channel();
  (CallbackSender { sender }, receiver)
}
