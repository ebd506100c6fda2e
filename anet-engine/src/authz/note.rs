//! Free-text note authorization
//!
//! Notes carry no recurrence: anyone may create and read them, only their
//! author (or an administrator) may change or delete them.

use super::{Actor, Decision, Operation};
use crate::db::notes::Note;

pub fn authorize_note(actor: &Actor, note: &Note, operation: Operation) -> Decision {
    match operation {
        Operation::Create | Operation::Read => Decision::Allow,
        Operation::Update | Operation::Delete => {
            Decision::from(actor.is_privileged() || note.author_uuid == actor.person_uuid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::ActorPosition;
    use anet_common::enums::PositionType;
    use uuid::Uuid;

    fn person(position_type: PositionType) -> Actor {
        Actor {
            person_uuid: Uuid::new_v4(),
            position: Some(ActorPosition {
                uuid: Uuid::new_v4(),
                position_type,
                organization_uuid: None,
            }),
            is_system: false,
        }
    }

    #[test]
    fn test_anyone_creates_and_reads() {
        let note = Note::new(Uuid::new_v4(), "text");
        let other = person(PositionType::Regular);
        assert!(authorize_note(&other, &note, Operation::Create).is_allowed());
        assert!(authorize_note(&other, &note, Operation::Read).is_allowed());
    }

    #[test]
    fn test_only_author_or_admin_changes() {
        let author = person(PositionType::Regular);
        let note = Note::new(author.person_uuid, "text");
        let other = person(PositionType::Superuser);
        let admin = person(PositionType::Administrator);

        for operation in [Operation::Update, Operation::Delete] {
            assert!(authorize_note(&author, &note, operation).is_allowed());
            assert_eq!(authorize_note(&other, &note, operation), Decision::Deny);
            assert!(authorize_note(&admin, &note, operation).is_allowed());
        }
    }
}
