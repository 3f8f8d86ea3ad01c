// Общие константы формата GaldrDB.
//
// Файл БД — один файл, страницы фиксированного размера.
// Страница 0 — заголовок (см. header.rs), все смещения LE.

// ---- Заголовок файла (страница 0) ----

/// 4-байтовая магия файла ("GDB1").
pub const DB_MAGIC: &[u8; 4] = b"GDB1";
/// Версия формата.
pub const FORMAT_VERSION: u16 = 1;

pub const HDR_OFF_MAGIC: usize = 0x00;
pub const HDR_OFF_VERSION: usize = 0x04;
/// page_size (u16). Хранится по модулю 65536: значение 0 означает 65536.
pub const HDR_OFF_PAGE_SIZE: usize = 0x06;
pub const HDR_OFF_CATALOG_ROOT: usize = 0x08;
pub const HDR_OFF_FREE_HEAD: usize = 0x0C;
pub const HDR_OFF_NEXT_TX_ID: usize = 0x10;
pub const HDR_OFF_NEXT_PAGE_ID: usize = 0x18;
pub const HDR_OFF_FLAGS: usize = 0x1C;

/// flags bit0: WAL включён при создании БД.
pub const FLAG_WAL_ENABLED: u64 = 0x1;

/// Допустимые размеры страницы: степень двойки, 4 KiB..=64 KiB.
pub const MIN_PAGE_SIZE: u32 = 4096;
pub const MAX_PAGE_SIZE: u32 = 65536;

// ---- Типы страниц (первый байт каждой страницы, кроме страницы 0) ----

pub const PAGE_TYPE_DOCUMENT: u8 = 1;
pub const PAGE_TYPE_OVERFLOW: u8 = 2;
pub const PAGE_TYPE_FREE: u8 = 3;
pub const PAGE_TYPE_BTREE_LEAF: u8 = 4;
pub const PAGE_TYPE_BTREE_INTERNAL: u8 = 5;

/// "Нет страницы". Страница 0 — заголовок, ссылкой быть не может.
pub const NO_PAGE: u32 = 0;

// ---- Slotted-страница документов ----
//
// Заголовок (16 B):
// [page_type u8][reserved u8][slot_count u16][free_space_offset u16]
// [free_space_end u16][next_page_id u32][checksum u32]
//
// free_space_end хранится по модулю 65536 (0 == page_size при 64 KiB).

pub const SLOT_HDR_SIZE: usize = 16;
pub const SP_OFF_TYPE: usize = 0;
pub const SP_OFF_SLOT_COUNT: usize = 2;
pub const SP_OFF_FREE_START: usize = 4;
pub const SP_OFF_FREE_END: usize = 6;
pub const SP_OFF_NEXT_PAGE: usize = 8;
pub const SP_OFF_CHECKSUM: usize = 12;

// Слот (16 B):
// [offset u16][length u16][total_size u32][page_count u16][first_overflow u32][reserved u16]
//
// page_count считает домашнюю страницу плюс overflow-страницы:
//  - length>0, page_count=1  — документ целиком в странице;
//  - length=0, page_count>1  — документ целиком в overflow-цепочке;
//  - length=0, page_count=0  — tombstone.
pub const SLOT_ENTRY_SIZE: usize = 16;
pub const SE_OFF_OFFSET: usize = 0;
pub const SE_OFF_LENGTH: usize = 2;
pub const SE_OFF_TOTAL: usize = 4;
pub const SE_OFF_PAGE_COUNT: usize = 8;
pub const SE_OFF_FIRST_OVF: usize = 10;

/// Порог compaction по умолчанию (байт «мёртвого» места).
pub const COMPACTION_MIN_GAIN: usize = 64;

// ---- Overflow-страница ----
//
// [page_type u8][reserved u8][chunk_len u16][reserved u32], далее chunk.
// Цепочка занимает последовательные page_id, next-ссылка не нужна.

pub const OVF_HDR_SIZE: usize = 8;
pub const OVF_OFF_CHUNK_LEN: usize = 2;

// ---- Свободная страница ----
//
// [page_type u8][pad 3][next_free u32], остальное не значимо.

pub const FREE_OFF_NEXT: usize = 4;

// ---- Узел B+-дерева ----
//
// Заголовок (16 B):
// [node_type u8][reserved u8][key_count u16][order u16][next_leaf u32]
// [parent u32][reserved u16]
//
// next_leaf: у листьев — правый сосед; у внутренних узлов в этом же поле
// хранится правый (крайний) ребёнок. parent — подсказка, не авторитет:
// канонический родитель определяется спуском от корня.

pub const BT_HDR_SIZE: usize = 16;
pub const BT_OFF_TYPE: usize = 0;
pub const BT_OFF_KEY_COUNT: usize = 2;
pub const BT_OFF_ORDER: usize = 4;
pub const BT_OFF_NEXT: usize = 6;
pub const BT_OFF_PARENT: usize = 10;

/// Значение в листе: [page_id u32][slot u16][flags u8].
pub const BT_VALUE_SIZE: usize = 7;
/// Ссылка на ребёнка во внутреннем узле: u32.
pub const BT_CHILD_SIZE: usize = 4;

/// flags bit0 у значения листа первичного индекса: документ удалён.
pub const BT_VFLAG_DELETED: u8 = 0x1;

/// Кап на закодированный строковый ключ индекса (политика disallow-over-cap).
pub const STRING_KEY_MAX: usize = 32;

// ---- Документы ----

/// Префикс-конверт каждого payload: [doc_id u64 LE].
pub const DOC_ENVELOPE_SIZE: usize = 8;

// ---- Зарезервированные коллекции каталога ----

pub const CATALOG_COLLECTIONS: &str = "$collections";
pub const CATALOG_INDEXES: &str = "$indexes";

// ---- WAL ----

/// Заголовок WAL-файла (16 B): [magic8][checkpoint_tx_id u64].
pub const WAL_MAGIC: &[u8; 8] = b"GDB1WAL1";
pub const WAL_HDR_SIZE: usize = 16;

// Запись WAL:
// [commit_tx_id u64][page_id u32][length u32][after_image bytes[length]][crc32 u32]
//
// crc32 — по заголовку записи и образу. Запись с page_id=WAL_BARRIER и
// length=0 — барьер фиксации своей группы commit_tx_id: replay применяет
// только группы, завершённые барьером с корректным crc.
pub const WAL_REC_HDR_SIZE: usize = 16;
pub const WAL_REC_OFF_TX: usize = 0;
pub const WAL_REC_OFF_PAGE_ID: usize = 8;
pub const WAL_REC_OFF_LEN: usize = 12;
pub const WAL_BARRIER_PAGE_ID: u32 = u32::MAX;

// ---- Транзакции ----

/// Первый выдаваемый TxId; created_by=0 — «до открытия», видим всем снапшотам.
pub const FIRST_TX_ID: u64 = 1;

/// Каждые N коммитов счётчики заголовка сбрасываются на диск.
pub const HEADER_PERSIST_INTERVAL: u64 = 64;
