/// Both calls must be idempotent: the channel stops the alarm on every
/// teardown path, including ones where it never started.
pub trait AlarmSink: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

pub struct LogAlarm;

impl AlarmSink for LogAlarm {
    fn start(&self) {
        tracing::info!("dock alarm sounding");
    }

    fn stop(&self) {
        tracing::info!("dock alarm silenced");
    }
}
