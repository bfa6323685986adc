/// A field carried by a partial-update message: either left alone or replaced
/// wholesale. Built from the wire format's `update*` flag and value pair.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    Unchanged,
    Replace(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Unchanged
    }
}

impl<T> FieldUpdate<T> {
    pub fn from_flag(flag: bool, value: T) -> Self {
        if flag {
            FieldUpdate::Replace(value)
        } else {
            FieldUpdate::Unchanged
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, FieldUpdate::Replace(_))
    }

    pub fn as_replacement(&self) -> Option<&T> {
        match self {
            FieldUpdate::Replace(value) => Some(value),
            FieldUpdate::Unchanged => None,
        }
    }

    /// Writes the replacement into `target`. Returns whether anything changed.
    pub fn apply_to(self, target: &mut T) -> bool {
        match self {
            FieldUpdate::Replace(value) => {
                *target = value;
                true
            }
            FieldUpdate::Unchanged => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flag_leaves_target_alone() {
        let mut target = vec![1, 2];
        assert!(!FieldUpdate::from_flag(false, vec![]).apply_to(&mut target));
        assert_eq!(target, vec![1, 2]);

        assert!(FieldUpdate::from_flag(true, vec![]).apply_to(&mut target));
        assert!(target.is_empty());
    }
}
