//! Mock version of an item writer, for failure injection.
use mockall::mock;

use spring_batch_engine::core::item::{ItemWriter, ItemWriterResult};

mock! {
    pub Writer {}
    impl ItemWriter<String> for Writer {
        fn write(&self, items: &[String]) -> ItemWriterResult;
        fn flush(&self) -> ItemWriterResult;
        fn open(&self) -> ItemWriterResult;
        fn close(&self) -> ItemWriterResult;
    }
}

impl MockWriter {
    /// Mock whose lifecycle calls succeed; only `write` needs expectations.
    pub fn lenient() -> Self {
        let mut writer = MockWriter::new();
        writer.expect_open().returning(|| Ok(()));
        writer.expect_flush().returning(|| Ok(()));
        writer.expect_close().returning(|| Ok(()));
        writer
    }
}
