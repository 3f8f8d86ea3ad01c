//! btree/tree — операции дерева: спуск с бинарным поиском, вставка с
//! упреждающим расщеплением, range-обход по сцепке листьев.
//!
//! Полные узлы расщепляются по пути вниз (у родителя к моменту расщепления
//! ребёнка гарантированно есть место), поэтому подъёма по стеку нет.
//! Медиана листа копируется вверх (остаётся в правой половине), медиана
//! внутреннего узла переезжает вверх. Идентичность дерева — page_id его
//! корня; при расщеплении корня он меняется, вызывающий обязан проверить
//! root() после вставки.
//!
//! remove/update_value локальны листу: слияний и ребалансировки нет,
//! пустой лист остаётся в дереве и безвреден для поиска и обхода.

use crate::consts::NO_PAGE;
use crate::errors::{GaldrError, Result};
use crate::metrics::record_btree_split;
use crate::pager::PageAccess;

use super::node::{
    internal_child, internal_insert_at, internal_key, internal_set_child, leaf_insert_at,
    leaf_key, leaf_remove_at, leaf_set_value, leaf_value, node_init, node_is_leaf,
    node_key_count, node_next, node_order, node_set_key_count, node_set_next, node_set_parent,
    LeafValue,
};

pub struct BTree<'a> {
    access: &'a mut dyn PageAccess,
    root: u32,
    key_width: usize,
}

impl<'a> BTree<'a> {
    /// Новое дерево: один пустой лист. Возвращает page_id корня.
    pub fn create(access: &mut dyn PageAccess, key_width: usize) -> Result<u32> {
        let pid = access.allocate()?;
        let mut page = vec![0u8; access.page_size() as usize];
        node_init(&mut page, true, key_width);
        access.write(pid, &page)?;
        Ok(pid)
    }

    pub fn open(access: &'a mut dyn PageAccess, root: u32, key_width: usize) -> Self {
        Self {
            access,
            root,
            key_width,
        }
    }

    /// Текущий корень (меняется при расщеплении корня).
    pub fn root(&self) -> u32 {
        self.root
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_width {
            return Err(GaldrError::invalid_arg(format!(
                "key length {} != index key width {}",
                key.len(),
                self.key_width
            )));
        }
        Ok(())
    }

    fn load(&mut self, pid: u32) -> Result<Vec<u8>> {
        let page = self.access.read(pid)?;
        node_is_leaf(&page)?;
        Ok(page)
    }

    /// Первый индекс i листа с key_i >= key.
    fn leaf_lower_bound(&self, page: &[u8], key: &[u8]) -> u16 {
        let n = node_key_count(page);
        let (mut lo, mut hi) = (0u16, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if leaf_key(page, self.key_width, mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Позиция ребёнка для спуска: первый i с key < key_i, иначе правый.
    fn child_pos(&self, page: &[u8], key: &[u8]) -> u16 {
        let n = node_key_count(page);
        let (mut lo, mut hi) = (0u16, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if key < internal_key(page, self.key_width, mid) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    fn child_at(&self, page: &[u8], pos: u16) -> u32 {
        if pos == node_key_count(page) {
            node_next(page)
        } else {
            internal_child(page, self.key_width, pos)
        }
    }

    /// Спуск от корня к листу.
    fn find_leaf(&mut self, key: &[u8]) -> Result<(u32, Vec<u8>)> {
        let mut pid = self.root;
        let mut page = self.load(pid)?;
        loop {
            if node_is_leaf(&page)? {
                return Ok((pid, page));
            }
            let pos = self.child_pos(&page, key);
            let child = self.child_at(&page, pos);
            if child == NO_PAGE {
                return Err(GaldrError::corruption(format!(
                    "internal node {} has no child at position {}",
                    pid, pos
                )));
            }
            pid = child;
            page = self.load(pid)?;
        }
    }

    pub fn search(&mut self, key: &[u8]) -> Result<Option<LeafValue>> {
        self.check_key(key)?;
        let (_pid, leaf) = self.find_leaf(key)?;
        let pos = self.leaf_lower_bound(&leaf, key);
        if pos < node_key_count(&leaf) && leaf_key(&leaf, self.key_width, pos) == key {
            return Ok(Some(leaf_value(&leaf, self.key_width, pos)));
        }
        Ok(None)
    }

    /// Расщепить полного ребёнка child (на позиции pos родителя parent).
    /// Родитель не полон. Обе половины и родитель записываются.
    fn split_child(
        &mut self,
        parent: &mut [u8],
        parent_pid: u32,
        pos: u16,
        child_pid: u32,
        mut child: Vec<u8>,
    ) -> Result<()> {
        let kw = self.key_width;
        let n = node_key_count(&child);
        let mid = n / 2;
        let right_pid = self.access.allocate()?;
        let mut right = vec![0u8; child.len()];
        let leaf = node_is_leaf(&child)?;

        let separator: Vec<u8>;
        if leaf {
            node_init(&mut right, true, kw);
            separator = leaf_key(&child, kw, mid).to_vec();
            // Медиана копируется вверх и остаётся первой в правой половине.
            for i in mid..n {
                let k = leaf_key(&child, kw, i).to_vec();
                let v = leaf_value(&child, kw, i);
                leaf_insert_at(&mut right, kw, i - mid, &k, v);
            }
            node_set_key_count(&mut child, mid);
            // Сцепка листьев для range-сканов.
            node_set_next(&mut right, node_next(&child));
            node_set_next(&mut child, right_pid);
        } else {
            node_init(&mut right, false, kw);
            separator = internal_key(&child, kw, mid).to_vec();
            // Медиана переезжает вверх; её ребёнок становится правым у левой
            // половины.
            for i in mid + 1..n {
                let k = internal_key(&child, kw, i).to_vec();
                let c = internal_child(&child, kw, i);
                internal_insert_at(&mut right, kw, i - mid - 1, &k, c);
            }
            let old_rightmost = node_next(&child);
            node_set_next(&mut right, old_rightmost);
            let mid_child = internal_child(&child, kw, mid);
            node_set_next(&mut child, mid_child);
            node_set_key_count(&mut child, mid);
        }

        // Вставить (separator, левая половина) в родителя.
        let pn = node_key_count(parent);
        if pos == pn {
            internal_insert_at(parent, kw, pos, &separator, child_pid);
            node_set_next(parent, right_pid);
        } else {
            internal_insert_at(parent, kw, pos, &separator, child_pid);
            internal_set_child(parent, kw, pos + 1, right_pid);
        }

        node_set_parent(&mut child, parent_pid);
        node_set_parent(&mut right, parent_pid);

        self.access.write(child_pid, &child)?;
        self.access.write(right_pid, &right)?;
        self.access.write(parent_pid, parent)?;
        record_btree_split();
        Ok(())
    }

    /// Вставка; дубликаты ключей запрещены.
    pub fn insert(&mut self, key: &[u8], value: LeafValue) -> Result<()> {
        self.check_key(key)?;
        let kw = self.key_width;
        let ps = self.access.page_size() as usize;

        // Полный корень расщепляется заранее: новый корень с одним правым
        // ребёнком, затем обычный путь.
        let root_buf = self.load(self.root)?;
        if node_key_count(&root_buf) == node_order(&root_buf) {
            let new_root_pid = self.access.allocate()?;
            let mut new_root = vec![0u8; ps];
            node_init(&mut new_root, false, kw);
            node_set_next(&mut new_root, self.root);
            self.split_child(&mut new_root, new_root_pid, 0, self.root, root_buf)?;
            self.root = new_root_pid;
        }

        let mut cur_pid = self.root;
        let mut cur = self.load(cur_pid)?;
        loop {
            if node_is_leaf(&cur)? {
                let pos = self.leaf_lower_bound(&cur, key);
                if pos < node_key_count(&cur) && leaf_key(&cur, kw, pos) == key {
                    return Err(GaldrError::invalid_op(format!(
                        "duplicate key in index (root {})",
                        self.root
                    )));
                }
                leaf_insert_at(&mut cur, kw, pos, key, value);
                self.access.write(cur_pid, &cur)?;
                return Ok(());
            }

            let mut pos = self.child_pos(&cur, key);
            let mut child_pid = self.child_at(&cur, pos);
            let mut child = self.load(child_pid)?;
            if node_key_count(&child) == node_order(&child) {
                self.split_child(&mut cur, cur_pid, pos, child_pid, child)?;
                pos = self.child_pos(&cur, key);
                child_pid = self.child_at(&cur, pos);
                child = self.load(child_pid)?;
            }
            cur_pid = child_pid;
            cur = child;
        }
    }

    /// Заменить значение существующего ключа. false — ключа нет.
    pub fn update_value(&mut self, key: &[u8], value: LeafValue) -> Result<bool> {
        self.check_key(key)?;
        let (pid, mut leaf) = self.find_leaf(key)?;
        let pos = self.leaf_lower_bound(&leaf, key);
        if pos < node_key_count(&leaf) && leaf_key(&leaf, self.key_width, pos) == key {
            leaf_set_value(&mut leaf, self.key_width, pos, value);
            self.access.write(pid, &leaf)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Удалить ключ из листа (без слияний). false — ключа нет.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let (pid, mut leaf) = self.find_leaf(key)?;
        let pos = self.leaf_lower_bound(&leaf, key);
        if pos < node_key_count(&leaf) && leaf_key(&leaf, self.key_width, pos) == key {
            leaf_remove_at(&mut leaf, self.key_width, pos);
            self.access.write(pid, &leaf)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Обход [lo, hi] включительно в порядке возрастания ключей.
    /// Колбэк возвращает false для досрочной остановки.
    pub fn for_each_range(
        &mut self,
        lo: &[u8],
        hi: &[u8],
        f: &mut dyn FnMut(&[u8], LeafValue) -> Result<bool>,
    ) -> Result<()> {
        self.check_key(lo)?;
        self.check_key(hi)?;
        let kw = self.key_width;

        let (_pid, mut leaf) = self.find_leaf(lo)?;
        let mut idx = self.leaf_lower_bound(&leaf, lo);
        loop {
            let n = node_key_count(&leaf);
            while idx < n {
                let key = leaf_key(&leaf, kw, idx);
                if key > hi {
                    return Ok(());
                }
                let v = leaf_value(&leaf, kw, idx);
                if !f(key, v)? {
                    return Ok(());
                }
                idx += 1;
            }
            let next = node_next(&leaf);
            if next == NO_PAGE {
                return Ok(());
            }
            leaf = self.load(next)?;
            idx = 0;
        }
    }

    /// Полный обход дерева.
    pub fn for_each(
        &mut self,
        f: &mut dyn FnMut(&[u8], LeafValue) -> Result<bool>,
    ) -> Result<()> {
        let lo = vec![0u8; self.key_width];
        let hi = vec![0xFFu8; self.key_width];
        self.for_each_range(&lo, &hi, f)
    }

    /// Все страницы дерева (достижимые от корня) — для doctor/orphans.
    pub fn collect_pages(&mut self) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(pid) = stack.pop() {
            let page = self.load(pid)?;
            out.push(pid);
            if !node_is_leaf(&page)? {
                let n = node_key_count(&page);
                for i in 0..n {
                    stack.push(internal_child(&page, self.key_width, i));
                }
                stack.push(node_next(&page));
            }
        }
        Ok(out)
    }

    /// Проверка инвариантов: строгий порядок ключей при обходе и равная
    /// глубина всех листьев. Возвращает (число ключей, глубина).
    pub fn verify(&mut self) -> Result<(u64, u32)> {
        let mut keys = 0u64;
        let mut prev: Option<Vec<u8>> = None;
        self.for_each(&mut |k, _v| {
            if let Some(p) = &prev {
                if k <= p.as_slice() {
                    return Err(GaldrError::corruption(
                        "btree keys out of order in leaf traversal",
                    ));
                }
            }
            prev = Some(k.to_vec());
            keys += 1;
            Ok(true)
        })?;

        let mut depth = 0u32;
        let mut depths: Vec<u32> = Vec::new();
        self.leaf_depths(self.root, 0, &mut depths)?;
        if let Some(&d0) = depths.first() {
            if depths.iter().any(|&d| d != d0) {
                return Err(GaldrError::corruption("btree leaves at differing depths"));
            }
            depth = d0;
        }
        Ok((keys, depth))
    }

    fn leaf_depths(&mut self, pid: u32, depth: u32, out: &mut Vec<u32>) -> Result<()> {
        let page = self.load(pid)?;
        if node_is_leaf(&page)? {
            out.push(depth);
            return Ok(());
        }
        let n = node_key_count(&page);
        for i in 0..n {
            let c = internal_child(&page, self.key_width, i);
            self.leaf_depths(c, depth + 1, out)?;
        }
        self.leaf_depths(node_next(&page), depth + 1, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::key::primary_key;
    use crate::errors::Result;
    use crate::io::{MemIo, PageIo};
    use crate::version::DocumentLocation;

    /// Простой PageAccess поверх MemIo для unit-тестов дерева.
    struct RawPages {
        io: MemIo,
        next: u32,
    }

    impl RawPages {
        fn new(ps: u32) -> Self {
            Self {
                io: MemIo::new(ps),
                next: 1,
            }
        }
    }

    impl PageAccess for RawPages {
        fn page_size(&self) -> u32 {
            self.io.page_size()
        }

        fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
            let mut buf = vec![0u8; self.page_size() as usize];
            crate::io::PageIo::read_page(&self.io, page_id, &mut buf)?;
            Ok(buf)
        }

        fn write(&mut self, page_id: u32, page: &[u8]) -> Result<()> {
            crate::io::PageIo::write_page(&self.io, page_id, page)
        }

        fn allocate(&mut self) -> Result<u32> {
            let pid = self.next;
            self.next += 1;
            Ok(pid)
        }

        fn allocate_consecutive(&mut self, count: u32) -> Result<u32> {
            let pid = self.next;
            self.next += count;
            Ok(pid)
        }
    }

    fn loc(p: u32, s: u16) -> LeafValue {
        LeafValue::new(DocumentLocation { page_id: p, slot: s })
    }

    #[test]
    fn insert_search_thousands_with_splits() {
        let mut pages = RawPages::new(4096);
        let root = BTree::create(&mut pages, 9).unwrap();
        let mut tree = BTree::open(&mut pages, root, 9);

        // Перемешанный порядок вставки.
        let n = 2000u64;
        let mut ids: Vec<u64> = (0..n).collect();
        let mut seed = 0x9E3779B97F4A7C15u64;
        for i in (1..ids.len()).rev() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (seed % (i as u64 + 1)) as usize;
            ids.swap(i, j);
        }
        for id in &ids {
            tree.insert(&primary_key(*id), loc(*id as u32 + 10, (*id % 7) as u16))
                .unwrap();
        }
        // Корень сменился: были расщепления.
        assert_ne!(tree.root(), root);

        for id in 0..n {
            let v = tree.search(&primary_key(id)).unwrap().expect("present");
            assert_eq!(v.page_id, id as u32 + 10);
            assert_eq!(v.slot, (id % 7) as u16);
        }
        assert!(tree.search(&primary_key(n + 1)).unwrap().is_none());

        // Порядок ключей и равная глубина листьев.
        let (keys, depth) = tree.verify().unwrap();
        assert_eq!(keys, n);
        assert!(depth >= 1);
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut pages = RawPages::new(4096);
        let root = BTree::create(&mut pages, 9).unwrap();
        let mut tree = BTree::open(&mut pages, root, 9);
        tree.insert(&primary_key(1), loc(1, 0)).unwrap();
        assert!(tree.insert(&primary_key(1), loc(2, 0)).is_err());
    }

    #[test]
    fn range_scan_is_ordered_and_bounded() {
        let mut pages = RawPages::new(4096);
        let root = BTree::create(&mut pages, 9).unwrap();
        let mut tree = BTree::open(&mut pages, root, 9);
        for id in (0..1000u64).rev() {
            tree.insert(&primary_key(id), loc(id as u32, 0)).unwrap();
        }

        let mut seen = Vec::new();
        tree.for_each_range(&primary_key(100), &primary_key(199), &mut |k, _v| {
            seen.push(crate::btree::key::doc_id_from_primary(k));
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, (100..=199).collect::<Vec<_>>());
    }

    #[test]
    fn update_and_remove_are_leaf_local() {
        let mut pages = RawPages::new(4096);
        let root = BTree::create(&mut pages, 9).unwrap();
        let mut tree = BTree::open(&mut pages, root, 9);
        for id in 0..500u64 {
            tree.insert(&primary_key(id), loc(id as u32, 0)).unwrap();
        }

        assert!(tree.update_value(&primary_key(42), loc(900, 3)).unwrap());
        assert_eq!(tree.search(&primary_key(42)).unwrap().unwrap().page_id, 900);
        assert!(!tree.update_value(&primary_key(9999), loc(1, 1)).unwrap());

        assert!(tree.remove(&primary_key(42)).unwrap());
        assert!(tree.search(&primary_key(42)).unwrap().is_none());
        assert!(!tree.remove(&primary_key(42)).unwrap());

        let (keys, _) = tree.verify().unwrap();
        assert_eq!(keys, 499);
    }
}
