/// Named data-change notifications, fired synchronously after a successful
/// write. Listeners run in registration order on the caller's thread; there
/// is no queue and no replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AttendanceUpdated,
    TeachingLogsUpdated,
    UsersUpdated,
    StudentsUpdated,
    ClassesUpdated,
    SubjectsUpdated,
    SchedulesUpdated,
    SettingsUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AttendanceUpdated => "attendanceUpdated",
            EventKind::TeachingLogsUpdated => "teachingLogsUpdated",
            EventKind::UsersUpdated => "usersUpdated",
            EventKind::StudentsUpdated => "studentsUpdated",
            EventKind::ClassesUpdated => "classesUpdated",
            EventKind::SubjectsUpdated => "subjectsUpdated",
            EventKind::SchedulesUpdated => "schedulesUpdated",
            EventKind::SettingsUpdated => "settingsUpdated",
        }
    }
}

type Listener = Box<dyn Fn(EventKind)>;

#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl Fn(EventKind) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&self, kind: EventKind) {
        tracing::debug!(event = kind.as_str(), "emit");
        for listener in &self.listeners {
            listener(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_fire_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        for tag in ["first", "second"] {
            let seen = Rc::clone(&seen);
            bus.subscribe(move |kind| seen.borrow_mut().push((tag, kind)));
        }
        bus.emit(EventKind::AttendanceUpdated);
        assert_eq!(
            *seen.borrow(),
            vec![
                ("first", EventKind::AttendanceUpdated),
                ("second", EventKind::AttendanceUpdated)
            ]
        );
    }
}
