use std::ops::Range;

use crate::{error::Result, store::SequenceStore};

/// Number of records handed to a processor between two [`ParallelProcessor::on_batch_complete`] calls
pub const BATCH_SIZE: u64 = 1024;

/// Trait for readers whose records can be processed in parallel
///
/// This is implemented by the **reader** not by the **processor**.
/// For the **processor**, see the [`ParallelProcessor`] trait.
///
/// Every thread works on its own [`SequenceStore::copy`] of the reader, so no
/// seek state is ever shared between threads.
pub trait ParallelReader {
    fn process_parallel<P: ParallelProcessor + 'static>(
        &self,
        processor: P,
        num_threads: usize,
    ) -> Result<()>;

    /// Process the records `range` (reader-relative ids) in parallel
    fn process_parallel_range<P: ParallelProcessor + 'static>(
        &self,
        processor: P,
        num_threads: usize,
        range: Range<u64>,
    ) -> Result<()>;
}

/// Trait for types that can process records in parallel.
///
/// This is implemented by the **processor** not by the **reader**.
/// For the **reader**, see the [`ParallelReader`] trait.
pub trait ParallelProcessor: Send + Clone {
    /// Process a single record
    ///
    /// `quality` is `None` if the store has no quality data.
    fn process_record(&mut self, id: u64, codes: &[u8], quality: Option<&[u8]>) -> Result<()>;

    /// Called when a thread finishes processing a batch
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each thread should call this method with its own unique ID.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

impl<S: SequenceStore + Send + 'static> ParallelReader for S {
    fn process_parallel<P: ParallelProcessor + 'static>(
        &self,
        processor: P,
        num_threads: usize,
    ) -> Result<()> {
        let num_records = self.number_records();
        self.process_parallel_range(processor, num_threads, 0..num_records)
    }

    fn process_parallel_range<P: ParallelProcessor + 'static>(
        &self,
        processor: P,
        num_threads: usize,
        range: Range<u64>,
    ) -> Result<()> {
        // Calculate the number of threads to use
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads.min(num_cpus::get())
        };

        let range = range.start..range.end.min(self.number_records());
        if range.start >= range.end {
            return Ok(()); // Nothing to process
        }
        let records_per_thread = (range.end - range.start).div_ceil(num_threads as u64);

        let mut handles = Vec::with_capacity(num_threads);
        for tid in 0..num_threads {
            let mut processor = processor.clone();
            let mut reader = self.copy()?;
            processor.set_tid(tid);

            let range = range.clone();
            let handle = std::thread::spawn(move || -> Result<()> {
                let start = range.start + tid as u64 * records_per_thread;
                let end = (start + records_per_thread).min(range.end);
                let has_quality = reader.has_quality();
                let mut codes = Vec::new();
                let mut quality = Vec::new();

                for batch_start in (start..end).step_by(BATCH_SIZE as usize) {
                    let batch_end = (batch_start + BATCH_SIZE).min(end);
                    for id in batch_start..batch_end {
                        let length = reader.length(id)? as usize;
                        codes.resize(length, 0);
                        reader.read(id, &mut codes)?;
                        let quality = if has_quality {
                            quality.resize(length, 0);
                            reader.read_quality(id, &mut quality)?;
                            Some(quality.as_slice())
                        } else {
                            None
                        };
                        processor.process_record(id, &codes, quality)?;
                    }
                    processor.on_batch_complete()?;
                }
                reader.close()
            });
            handles.push(handle);
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("A processing thread panicked"))??;
        }
        Ok(())
    }
}
