//! People, room occupants, and the identifier type that addresses either them or a room.

use std::{fmt, ops::Deref, sync::Arc};

use tokio::sync::OnceCell;
use tracing::{error, warn};

use crate::{
    base::{error::ApiResult, types::Res},
    service::api::{ApiClient, User},
};

use super::room::Room;

/// A person in kChat.
///
/// Profile details (username, email, full name) are fetched on first use and
/// shared by every clone of the person.
#[derive(Clone)]
pub struct Person {
    userid: String,
    channelid: Option<String>,
    teamid: Option<String>,
    api: ApiClient,
    profile: Arc<OnceCell<User>>,
}

impl Person {
    pub fn new(api: ApiClient, userid: impl Into<String>, channelid: Option<String>, teamid: Option<String>) -> Self {
        Self {
            userid: userid.into(),
            channelid,
            teamid,
            api,
            profile: Arc::new(OnceCell::new()),
        }
    }

    /// Creates a person whose profile is already known.
    pub fn with_profile(api: ApiClient, user: User, channelid: Option<String>, teamid: Option<String>) -> Self {
        Self {
            userid: user.id.clone(),
            channelid,
            teamid,
            api,
            profile: Arc::new(OnceCell::new_with(Some(user))),
        }
    }

    pub fn userid(&self) -> &str {
        &self.userid
    }

    /// The direct channel with this person, when known.
    pub fn channelid(&self) -> Option<&str> {
        self.channelid.as_deref()
    }

    pub fn teamid(&self) -> Option<&str> {
        self.teamid.as_deref()
    }

    /// The client of a person is the channel they talk through.
    pub fn client(&self) -> Option<&str> {
        self.channelid()
    }

    pub fn domain(&self) -> &str {
        self.api.domain()
    }

    async fn profile(&self) -> ApiResult<&User> {
        self.profile.get_or_try_init(|| self.api.get_user(&self.userid)).await
    }

    /// Cached username, if the profile has been loaded.
    pub fn cached_username(&self) -> Option<&str> {
        self.profile.get().map(|u| u.username.as_str()).filter(|u| !u.is_empty())
    }

    pub async fn username(&self) -> String {
        match self.profile().await {
            Ok(user) if !user.username.is_empty() => user.username.clone(),
            _ => {
                error!("Can't find username for user with ID {}", self.userid);
                format!("<{}>", self.userid)
            }
        }
    }

    pub async fn nick(&self) -> String {
        self.username().await
    }

    pub async fn email(&self) -> Res<String> {
        Ok(self.profile().await?.email.clone())
    }

    pub async fn fullname(&self) -> Res<String> {
        let user = self.profile().await?;

        if user.first_name.is_empty() {
            warn!("No first name for user with ID {}", self.userid);
        }

        if user.last_name.is_empty() {
            warn!("No surname for user with ID {}", self.userid);
        }

        Ok(format!("{} {}", user.first_name, user.last_name).trim().to_string())
    }

    /// The `@username` form used for mentions.
    pub async fn person(&self) -> String {
        format!("@{}", self.username().await)
    }

    /// The form matched against access lists (e.g., bot admins).
    pub async fn aclattr(&self) -> String {
        self.person().await
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cached_username() {
            Some(username) => write!(f, "@{username}"),
            None => write!(f, "@<{}>", self.userid),
        }
    }
}

impl fmt::Debug for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Person")
            .field("userid", &self.userid)
            .field("channelid", &self.channelid)
            .field("teamid", &self.teamid)
            .finish()
    }
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.userid == other.userid
    }
}

/// A person inside a room.
#[derive(Clone, Debug)]
pub struct RoomOccupant {
    person: Person,
    room: Room,
}

impl RoomOccupant {
    pub fn new(person: Person, room: Room) -> Self {
        Self { person, room }
    }

    pub fn person(&self) -> &Person {
        &self.person
    }

    pub fn room(&self) -> &Room {
        &self.room
    }
}

impl Deref for RoomOccupant {
    type Target = Person;

    fn deref(&self) -> &Self::Target {
        &self.person
    }
}

impl fmt::Display for RoomOccupant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.person.cached_username() {
            Some(username) => write!(f, "~{}/{}", self.room.name(), username),
            None => write!(f, "~{}/<{}>", self.room.name(), self.person.userid()),
        }
    }
}

impl PartialEq for RoomOccupant {
    fn eq(&self, other: &Self) -> bool {
        self.room == other.room && self.person.userid() == other.person.userid()
    }
}

/// Anything a message can come from or be sent to.
#[derive(Clone, Debug, PartialEq)]
pub enum Identifier {
    Person(Person),
    Room(Room),
    Occupant(RoomOccupant),
}

impl Identifier {
    /// The person behind this identifier, if it is not a room.
    pub fn as_person(&self) -> Option<&Person> {
        match self {
            Identifier::Person(person) => Some(person),
            Identifier::Occupant(occupant) => Some(occupant.person()),
            Identifier::Room(_) => None,
        }
    }

    pub fn userid(&self) -> Option<&str> {
        self.as_person().map(Person::userid)
    }

    pub fn is_room(&self) -> bool {
        matches!(self, Identifier::Room(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Person(person) => person.fmt(f),
            Identifier::Room(room) => room.fmt(f),
            Identifier::Occupant(occupant) => occupant.fmt(f),
        }
    }
}

impl From<Person> for Identifier {
    fn from(person: Person) -> Self {
        Identifier::Person(person)
    }
}

impl From<Room> for Identifier {
    fn from(room: Room) -> Self {
        Identifier::Room(room)
    }
}

impl From<RoomOccupant> for Identifier {
    fn from(occupant: RoomOccupant) -> Self {
        Identifier::Occupant(occupant)
    }
}
