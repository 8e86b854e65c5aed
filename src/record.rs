/// Contract for the data that flows between stages.
///
/// `append` concatenates another value onto this one; multi-input
/// transformers use it to build the per-slot history, and the default
/// aggregator merge uses it to fold partial results. A value reporting
/// `is_empty` is not forwarded to downstream channels.
pub trait Record: Clone + Default + Send + Sync + 'static {
    fn append(&mut self, other: &Self);

    fn is_empty(&self) -> bool {
        false
    }
}

impl Record for String {
    fn append(&mut self, other: &Self) {
        self.push_str(other);
    }

    fn is_empty(&self) -> bool {
        str::is_empty(self)
    }
}

impl<U> Record for Vec<U>
where
    U: Clone + Send + Sync + 'static,
{
    fn append(&mut self, other: &Self) {
        self.extend_from_slice(other);
    }

    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_append() {
        let mut history = String::default();
        history.append(&"B1".to_string());
        history.append(&"B2".to_string());
        assert_eq!(history, "B1B2");
        assert!(Record::is_empty(&String::new()));
        assert!(!Record::is_empty(&history));
    }

    #[test]
    fn test_vec_append() {
        let mut rows = vec![1, 2];
        Record::append(&mut rows, &vec![3]);
        assert_eq!(rows, vec![1, 2, 3]);
        assert!(Record::is_empty(&Vec::<i32>::new()));
    }
}
