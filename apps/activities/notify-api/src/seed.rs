//! The school's starting roster.

use chrono::{NaiveTime, Weekday};
use domain_notifications::{Activity, InMemoryActivityDirectory};

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Add one slot per weekday with the same hours.
fn meets(mut activity: Activity, days: &[Weekday], start: NaiveTime, end: NaiveTime) -> Activity {
    for day in days {
        activity = activity.with_meeting(*day, start, end);
    }
    activity
}

pub fn activities() -> Vec<Activity> {
    use Weekday::*;

    vec![
        meets(
            Activity::new(
                "Chess Club",
                "Learn strategies and compete in chess tournaments",
                "Fridays, 3:30 PM - 5:00 PM",
                12,
            ),
            &[Fri],
            hm(15, 30),
            hm(17, 0),
        )
        .with_participants(["michael@mergington.edu", "daniel@mergington.edu"]),
        meets(
            Activity::new(
                "Programming Class",
                "Learn programming fundamentals and build software projects",
                "Tuesdays and Thursdays, 3:30 PM - 4:30 PM",
                20,
            ),
            &[Tue, Thu],
            hm(15, 30),
            hm(16, 30),
        )
        .with_participants(["emma@mergington.edu", "sophia@mergington.edu"]),
        meets(
            Activity::new(
                "Gym Class",
                "Physical education and sports activities",
                "Mondays, Wednesdays, Fridays, 2:00 PM - 3:00 PM",
                30,
            ),
            &[Mon, Wed, Fri],
            hm(14, 0),
            hm(15, 0),
        )
        .with_participants(["john@mergington.edu", "olivia@mergington.edu"]),
        meets(
            Activity::new(
                "Soccer Team",
                "Join the school soccer team and compete in matches",
                "Tuesdays and Thursdays, 4:00 PM - 5:30 PM",
                22,
            ),
            &[Tue, Thu],
            hm(16, 0),
            hm(17, 30),
        )
        .with_participants(["liam@mergington.edu", "noah@mergington.edu"]),
        meets(
            Activity::new(
                "Basketball Team",
                "Practice and play basketball with the school team",
                "Wednesdays and Fridays, 3:30 PM - 5:00 PM",
                15,
            ),
            &[Wed, Fri],
            hm(15, 30),
            hm(17, 0),
        )
        .with_participants(["ava@mergington.edu", "mia@mergington.edu"]),
        meets(
            Activity::new(
                "Art Club",
                "Explore your creativity through painting and drawing",
                "Thursdays, 3:30 PM - 5:00 PM",
                15,
            ),
            &[Thu],
            hm(15, 30),
            hm(17, 0),
        )
        .with_participants(["amelia@mergington.edu", "harper@mergington.edu"]),
        meets(
            Activity::new(
                "Drama Club",
                "Act, direct, and produce plays and performances",
                "Mondays and Wednesdays, 4:00 PM - 5:30 PM",
                20,
            ),
            &[Mon, Wed],
            hm(16, 0),
            hm(17, 30),
        )
        .with_participants(["ella@mergington.edu", "scarlett@mergington.edu"]),
        meets(
            Activity::new(
                "Math Club",
                "Solve challenging problems and participate in math competitions",
                "Tuesdays, 3:30 PM - 4:30 PM",
                10,
            ),
            &[Tue],
            hm(15, 30),
            hm(16, 30),
        )
        .with_participants(["james@mergington.edu", "benjamin@mergington.edu"]),
        meets(
            Activity::new(
                "Debate Team",
                "Develop public speaking and argumentation skills",
                "Fridays, 4:00 PM - 5:30 PM",
                12,
            ),
            &[Fri],
            hm(16, 0),
            hm(17, 30),
        )
        .with_participants(["charlotte@mergington.edu", "henry@mergington.edu"]),
        meets(
            Activity::new(
                "GitHub Skills",
                "Learn practical coding and collaboration skills with GitHub - part of our GitHub Certifications program",
                "Wednesdays, 3:30 PM - 5:00 PM",
                25,
            ),
            &[Wed],
            hm(15, 30),
            hm(17, 0),
        ),
    ]
}

pub fn roster() -> InMemoryActivityDirectory {
    InMemoryActivityDirectory::with_activities(activities())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_activity_has_meetings() {
        let activities = activities();
        assert_eq!(activities.len(), 10);
        assert!(activities.iter().all(|a| !a.meetings.is_empty()));
        assert!(activities.iter().all(|a| a.participants.len() < a.max_participants));
    }
}
